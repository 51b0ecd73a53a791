pub mod baseline;
pub mod errors;
pub mod fitness;
pub mod history;
pub mod run;

pub use baseline::*;
pub use errors::*;
pub use fitness::*;
pub use history::*;
pub use run::*;
