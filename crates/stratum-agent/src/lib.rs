//! The per-node `stratum-agent` daemon: joins the fleet coordinator at
//! startup, then serves the `AgentFleet` RPCs the coordinator dials
//! back for (`Exec`/`Validate`/`CheckPorts`/`CheckBandwidth`/
//! `Shutdown`).

pub mod server;

pub use server::AgentServer;
