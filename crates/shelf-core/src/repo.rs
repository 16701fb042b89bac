use shelf_schema::PackageName;

/// A validated remote repository reference in `owner/repo` format.
///
/// # Example
///
/// ```
/// use shelf_core::repo::RepoSlug;
///
/// let repo = RepoSlug::new("bennr01/benterfaces").unwrap();
/// assert_eq!(repo.owner(), "bennr01");
/// assert_eq!(repo.name(), "benterfaces");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RepoSlug {
    owner: String,
    name: String,
}

impl RepoSlug {
    /// Create a new `RepoSlug`, validating the `owner/repo` format.
    ///
    /// # Errors
    ///
    /// Returns an error string if `s` does not contain exactly one `/` or if
    /// either component is empty or contains characters outside
    /// `[A-Za-z0-9._-]`.
    pub fn new(s: &str) -> Result<Self, String> {
        if let Some((owner, name)) = s.split_once('/') {
            if !name.contains('/')
                && PackageName::parse(owner).is_ok()
                && PackageName::parse(name).is_ok()
            {
                return Ok(Self {
                    owner: owner.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Err(format!("invalid repository reference: expected 'owner/repo', got '{s}'"))
    }

    /// Get the owner part.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Get the repo name part.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}
