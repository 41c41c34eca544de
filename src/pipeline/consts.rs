/// Item key holding the id of the processed marker of the current record.
pub const PROCESSED_ID_KEY: &str = "processed_id";
/// Item key holding the external id of the current record.
pub const RECORD_ID_KEY: &str = "record_id";
/// Item key set by workers to the slot they run in.
pub const SLOT_ID_KEY: &str = "slot_id";
/// Item key set by workers to their worker id.
pub const PROCESS_ID_KEY: &str = "process_id";
/// Property section configuring processed markers.
pub const PROCESSED_PROPERTY: &str = "processed";
/// Key of `data` under which a marker stores the item, unless configured.
pub const DEFAULT_PROCESSED_TARGET: &str = "result";
/// Marker messages are cut after this many characters.
pub const MARKER_MESSAGE_LIMIT: usize = 187;
