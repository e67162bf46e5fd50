use serde::Serialize;

pub const NPM: &str = "npm";
pub const TYPESCRIPT: &str = "typescript";
pub const TYPESCRIPT_LANGUAGE_SERVER: &str = "typescript-language-server";

/// Ordered packages kept installed and current inside the bundled runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AuxiliaryPackageSet {
    packages: Vec<String>,
}

impl AuxiliaryPackageSet {
    /// The packages shipped with every bundled runtime.
    #[must_use]
    pub fn bundled() -> Self {
        Self::new([NPM, TYPESCRIPT, TYPESCRIPT_LANGUAGE_SERVER])
    }

    #[must_use]
    pub fn new<I, S>(packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.packages.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

impl Default for AuxiliaryPackageSet {
    fn default() -> Self {
        Self::bundled()
    }
}
