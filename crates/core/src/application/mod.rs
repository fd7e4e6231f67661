// Application Layer - The persistor protocol built on the ports

pub mod persistor;

// Re-exports
pub use persistor::DefaultPersistor;
