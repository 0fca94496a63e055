diesel::table! {
    users (id) {
        id -> Int8,
        username -> Varchar,
        role -> Int2,
        admin_flags -> Int4,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    video_channels (id) {
        id -> Int8,
        name -> Varchar,
        owner_id -> Int8,
        actor_url -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    videos (id) {
        id -> Int8,
        uuid -> Uuid,
        name -> Varchar,
        category -> Nullable<Int4>,
        licence -> Nullable<Int4>,
        language -> Nullable<Varchar>,
        privacy -> Int2,
        nsfw -> Bool,
        description -> Nullable<Text>,
        support -> Nullable<Text>,
        wait_transcoding -> Bool,
        comments_enabled -> Bool,
        download_enabled -> Bool,
        state -> Int2,
        remote -> Bool,
        originally_published_at -> Nullable<Timestamptz>,
        published_at -> Timestamptz,
        channel_id -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    tags (id) {
        id -> Int8,
        name -> Varchar,
    }
}

diesel::table! {
    video_tags (video_id, tag_id) {
        video_id -> Int8,
        tag_id -> Int8,
    }
}

diesel::table! {
    thumbnails (id) {
        id -> Int8,
        video_id -> Int8,
        kind -> Int2,
        filename -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    video_streaming_playlists (id) {
        id -> Int8,
        video_id -> Int8,
        playlist_url -> Varchar,
    }
}

diesel::table! {
    video_files (id) {
        id -> Int8,
        video_id -> Nullable<Int8>,
        playlist_id -> Nullable<Int8>,
        resolution -> Int4,
        size -> Int8,
        extname -> Varchar,
        torrent_filename -> Nullable<Varchar>,
        info_hash -> Nullable<Varchar>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    schedule_video_updates (id) {
        id -> Int8,
        video_id -> Int8,
        update_at -> Timestamptz,
        privacy -> Nullable<Int2>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    video_blacklists (id) {
        id -> Int8,
        video_id -> Int8,
        reason -> Nullable<Text>,
        unfederated -> Bool,
        blacklist_type -> Int2,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_type -> Varchar,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        payload -> Jsonb,
        metadata -> Nullable<Jsonb>,
        created_at -> Timestamptz,
        published_at -> Nullable<Timestamptz>,
        retry_count -> Int4,
        last_error -> Nullable<Text>,
        seq -> Int8,
    }
}

diesel::joinable!(video_channels -> users (owner_id));
diesel::joinable!(videos -> video_channels (channel_id));
diesel::joinable!(video_tags -> videos (video_id));
diesel::joinable!(video_tags -> tags (tag_id));
diesel::joinable!(thumbnails -> videos (video_id));
diesel::joinable!(video_streaming_playlists -> videos (video_id));
diesel::joinable!(video_files -> video_streaming_playlists (playlist_id));
diesel::joinable!(schedule_video_updates -> videos (video_id));
diesel::joinable!(video_blacklists -> videos (video_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    video_channels,
    videos,
    tags,
    video_tags,
    thumbnails,
    video_streaming_playlists,
    video_files,
    schedule_video_updates,
    video_blacklists,
    outbox_events,
);
