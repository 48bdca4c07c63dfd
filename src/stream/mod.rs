pub mod backpressure;
pub mod blocksize;
pub mod byte_queue;
pub mod coordinator;
pub mod ledger;
pub mod properties;
pub mod signals;
pub mod sink;
pub mod state;

use crate::events::EventBus;

use coordinator::RequestCoordinator;
use state::SharedState;

/// Everything both sides of a source share. The network side only ever sees it through a
/// `Weak<dyn EventTarget>`.
pub(crate) struct Core {
    pub state: SharedState,
    pub events: EventBus,
    pub coordinator: RequestCoordinator,
}
