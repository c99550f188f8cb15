// Worker constants (no magic values)
use std::time::Duration;

/// Poll interval for pending jobs when nothing was dispatched (250ms)
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sleep duration after worker error before retry (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Capacity of the submit -> worker dispatch channel
pub const DISPATCH_CHANNEL_CAPACITY: usize = 256;

/// Detail recorded on jobs failed by crash recovery
pub const INTERRUPTED_DETAIL: &str = "interrupted: worker stopped before the job finished";

/// Key prefix for rendered outputs in the artifact store
pub const OUTPUT_KEY_PREFIX: &str = "outputs";
