use super::{SampleLog, SampleRecord};
use ccsim_core::{
    SimTime,
    clock::{EventId, Scheduler},
    interface::InterfaceId,
    network::Network,
};
use std::{cell::RefCell, rc::Rc};
use tracing::trace;

/// Samples the depth of the queue discipline of `interface` every
/// `interval`, from time zero until the clock stops.
#[derive(Debug, Clone)]
pub struct QueueSampler {
    pub interface: InterfaceId,
    pub interval: SimTime,
    pub log: Rc<RefCell<SampleLog>>,
}

impl QueueSampler {
    pub fn schedule(self, scheduler: &mut Scheduler<Network>) -> EventId {
        let Self {
            interface,
            interval,
            log,
        } = self;

        scheduler.schedule_recurring(
            SimTime::ZERO,
            interval,
            "queue-sample",
            move |scheduler, network| {
                // an interface without a discipline has nothing to report
                let Some(queue_disc) = network.queue_disc(interface) else {
                    return Ok(());
                };
                let record = SampleRecord {
                    time: scheduler.now(),
                    depth: queue_disc.current_size().value(),
                };
                trace!(iface = %interface, %record, "queue sample");
                log.borrow_mut().append(record)?;
                Ok(())
            },
        )
    }
}
