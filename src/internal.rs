mod dispatcher;
mod gate;
mod history;
mod registry;
mod replayer;

pub(crate) use dispatcher::{Delivery, Dispatcher};
pub(crate) use gate::ConcurrencyGate;
pub(crate) use history::EventHistory;
pub(crate) use registry::Registry;
pub(crate) use replayer::spawn_replayer;
