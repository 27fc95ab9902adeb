//! Gateway access and on-disk state: checkpoints and contract files.

pub mod checkpoint;
pub mod gateway;
pub mod parquet;
pub mod provider;
pub mod writer;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use gateway::GatewayClient;
pub use parquet::{write_parquet, ParquetError};
pub use provider::{ApiError, HistoricalRequest, MarketDataApi};
pub use writer::{ContractFileWriter, ContractRows, WriterError};
