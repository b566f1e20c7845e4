// Состояние сессии сопряжения: автомат, реестр живой сессии, события, драйвер

pub mod events;
pub mod machine;
pub mod registry;
pub mod session;

pub use events::{EventSink, SessionEvent};
pub use machine::{SocketState, SocketStateMachine};
pub use registry::{CancelSignal, SocketLease, SocketRegistry};
pub use session::{PairingSession, RequestContext, SessionDeps, SessionOutcome};
