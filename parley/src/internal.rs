mod peer_controller;
mod step_handler;

pub(crate) use peer_controller::{Attachment, PeerController};
pub(crate) use step_handler::StepHandler;
