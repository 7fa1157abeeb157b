mod limiter;
mod orchestrator;
mod support;
