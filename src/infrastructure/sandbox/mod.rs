mod process;

pub use process::ProcessSandbox;
