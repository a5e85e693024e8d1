//! The root crate's half of C1: the cluster-replicated backend. The
//! local (per-host) backend lives entirely in
//! [`stratum_common::store::LocalStore`] and needs nothing from this
//! crate; this module only adds the gRPC client side, which can't live
//! in `stratum-common` without a dependency cycle on `stratum-proto`.

mod cluster;

pub use cluster::ClusterStoreBackend;
