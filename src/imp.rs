// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//at the moment the only built-in backend is nop

use crate::config::BackendKind;
use crate::driver::Driver;

mod nop;

pub use nop::NopDriver;

/// Instantiates the built-in backend for `kind`.
pub(crate) fn driver_for(kind: BackendKind) -> Box<dyn Driver> {
    match kind {
        BackendKind::Nop => Box::new(NopDriver::new()),
    }
}
