use lazy_static::lazy_static;

lazy_static! {
    pub static ref ZCHANNEL_NUM_SIGNATURES_GENERATED: prometheus::IntCounter =
        prometheus::register_int_counter!(
            "zchannel_num_signatures_generated",
            "Number of distributed signatures this party took part in"
        )
        .unwrap();
}

lazy_static! {
    pub static ref ZCHANNEL_SIGNATURE_TIME_MS: prometheus::IntGauge =
        prometheus::register_int_gauge!(
            "zchannel_signature_time_ms",
            "Time taken by the last distributed signature"
        )
        .unwrap();
}

lazy_static! {
    pub static ref ZCHANNEL_NUM_UPDATES: prometheus::IntCounter =
        prometheus::register_int_counter!(
            "zchannel_num_updates",
            "Number of balance updates completed"
        )
        .unwrap();
}

lazy_static! {
    pub static ref ZCHANNEL_MESSAGES_SENT: prometheus::IntCounter =
        prometheus::register_int_counter!(
            "zchannel_messages_sent",
            "Number of wire messages handed to the transport"
        )
        .unwrap();
}

lazy_static! {
    pub static ref ZCHANNEL_MESSAGES_RECEIVED: prometheus::IntCounter =
        prometheus::register_int_counter!(
            "zchannel_messages_received",
            "Number of wire messages accepted into the inbox"
        )
        .unwrap();
}

lazy_static! {
    pub static ref ZCHANNEL_MESSAGES_DROPPED: prometheus::IntCounter =
        prometheus::register_int_counter!(
            "zchannel_messages_dropped",
            "Number of wire messages dropped as replays or duplicates"
        )
        .unwrap();
}
