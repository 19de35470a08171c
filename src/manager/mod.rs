//! Manager side: process table, port allocation, worker spawning, liveness
//! monitoring, and the [`Supervisor`](supervisor::Supervisor) façade.

pub mod monitor;
pub mod ports;
pub mod spawner;
pub mod supervisor;
pub mod table;
