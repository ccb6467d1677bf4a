pub mod provisioner;
pub mod responder;

pub use provisioner::{DatabaseProvisioner, Provisioned, Provisioner};
pub use responder::ResponseSender;
