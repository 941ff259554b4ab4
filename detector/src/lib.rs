pub mod background;
pub mod diff;
pub mod filter;
pub mod fusion;
pub mod job;
pub mod preprocess;
pub mod preview;
pub mod processor;
pub mod roi;
pub mod session;
pub mod source;
pub mod speed;
pub mod storage;
pub mod trigger;
