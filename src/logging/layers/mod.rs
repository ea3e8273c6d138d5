use tracing_subscriber::layer::Layer;

pub mod console;
pub mod file;
pub mod opentelemetry;

/// Boxed layer type so optional sinks can be collected uniformly.
pub type BoxLayer<S> = Box<dyn Layer<S> + Send + Sync>;
