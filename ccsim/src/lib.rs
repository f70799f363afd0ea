/*!
# Congestion control comparison harness

Builds a three node dumbbell (`sender`, `router`, `receiver`) on top of
[`ccsim_core`], sizes the bottleneck queue from the bandwidth-delay
product of the path, runs one bulk TCP transfer with the chosen
congestion control under a simulated or a kernel network stack, and
records the bottleneck queue depth and the sender's socket state while
it runs.

```no_run
use ccsim::{config::ExperimentConfig, driver::Experiment};

let config = ExperimentConfig {
    stack: "ns3".to_owned(),
    transport_prot: "westwood-plus".to_owned(),
    ..Default::default()
};
let report = Experiment::new(config)?.run()?;
println!("{report}");
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

pub mod buffer;
pub mod config;
pub mod congestion;
pub mod defaults;
pub mod driver;
mod error;
pub mod instrument;
pub mod output;
pub mod queue;
pub mod stack;
pub mod topology;
pub mod traffic;

pub use self::{
    config::ExperimentConfig,
    driver::{Experiment, RunReport},
    error::{ConfigError, RunError},
};
