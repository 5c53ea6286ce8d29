//! Read-only HTTP admin/snapshot surface (spec.md §6). Bound only when
//! `AppConfig.server.admin_enabled` is true (`NEXO_ENV` is not `prod`).

mod routes;
mod server;

pub use server::run;
