pub mod bootstrap;
pub mod cli;
pub mod logging;
pub mod publish;
pub mod run;
pub mod train;
