pub mod controller;
pub mod export;
pub mod registry;
pub mod storage;

pub use controller::ClusterController;
pub use export::ExportFormat;
pub use registry::ClusterRegistry;
pub use storage::ClusterStorage;
