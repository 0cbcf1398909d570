pub mod gen_logs;
pub mod replay;
