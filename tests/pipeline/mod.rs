mod data_flow;
mod runner;
mod shutdown;
