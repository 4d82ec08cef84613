pub use crate::server::{run_metrics_server, MetricsServerConfig};

mod server;
