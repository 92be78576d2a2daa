use std::sync::Mutex;

// Serializes tests that mutate process-wide environment variables
// (e.g. SKEIN_CONFIG).
pub static ENV_LOCK: Mutex<()> = Mutex::new(());
