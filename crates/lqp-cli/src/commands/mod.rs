pub mod dispatch;
pub mod sensitivity;
pub mod sweep;
pub mod validate;

use lqp_core::Diagnostics;
use tracing::warn;

/// Log every import issue at warn level.
pub fn log_diagnostics(diag: &Diagnostics) {
    for issue in diag.warnings().chain(diag.errors()) {
        warn!("{}", issue);
    }
}
