mod bind;
mod command_id;
mod command_status;
mod submit_sm;
mod tlv;

pub use bind::{BindRequest, BindResponse, BindType, SMPP_V34};
pub use command_id::CommandId;
pub use command_status::CommandStatus;
pub use submit_sm::SubmitSmResponse;
pub use tlv::Tlv;
