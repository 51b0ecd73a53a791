use crate::errors::FdmResult;

/// Source of known-good design vectors used for warm starts.
///
/// Unknown names fail with a configuration error.
pub trait BaselineProvider {
    fn get(&self, name: &str) -> FdmResult<Vec<f64>>;

    /// Fail fast on any name the provider cannot serve.
    fn validate(&self, names: &[String]) -> FdmResult<()> {
        for name in names {
            self.get(name)?;
        }
        Ok(())
    }
}
