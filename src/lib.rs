pub mod attacks;
pub mod metrics;
pub mod scenario;
pub mod session;

pub use attacks::{ActiveAttack, AttackKind};
pub use metrics::MetricsCollector;
pub use scenario::{RunMode, ScenarioConfig, ScenarioRunner};
pub use session::{SimSession, TrafficSession, VehicleId};

pub mod prelude {
    pub use crate::attacks::{ActiveAttack, AttackKind, Selection, Zone};
    pub use crate::metrics::MetricsCollector;
    pub use crate::scenario::{RunMode, ScenarioConfig, ScenarioRunner};
    pub use crate::session::{Collision, SimSession, TrafficSession, VehicleId};
}
