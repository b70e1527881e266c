pub mod protocol;
pub mod session;
pub mod sim;

pub use protocol::frame_codec::{CommandType, MotorAddress};
pub use protocol::param_table::{ParameterSpec, ParameterType, RunMode};
pub use protocol::response::ParameterValue;
pub use protocol::transport::{RawFrame, SharedTransport, Transport, TransportError};
pub use session::{MotorConfig, MotorError, MotorSession};
