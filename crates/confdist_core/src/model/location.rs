//! Owner-location binding for configuration records.
//!
//! # Invariants
//! - The effective location is the static location when set, otherwise the
//!   dynamic location.
//! - A dynamic binding is only established while no location is set.
//! - Setting a static location that differs from the dynamic one clears the
//!   dynamic one.

/// Result of a try-bind request. Both variants are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The record had no location and is now dynamically bound.
    Bound,
    /// A location already existed; nothing changed.
    AlreadyBound,
}

/// Static and dynamic owner locations of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationBinding {
    static_location: Option<String>,
    dynamic_location: Option<String>,
}

impl LocationBinding {
    pub fn new(static_location: Option<String>, dynamic_location: Option<String>) -> Self {
        Self {
            static_location,
            dynamic_location,
        }
    }

    pub fn static_location(&self) -> Option<&str> {
        self.static_location.as_deref()
    }

    pub fn dynamic_location(&self) -> Option<&str> {
        self.dynamic_location.as_deref()
    }

    pub fn effective(&self) -> Option<&str> {
        self.static_location
            .as_deref()
            .or(self.dynamic_location.as_deref())
    }

    /// Sets the static or dynamic location and returns the previous effective
    /// location.
    pub fn bind(&mut self, location: Option<String>, is_static: bool) -> Option<String> {
        let previous = self.effective().map(str::to_string);

        if is_static {
            let conflicts = match (&location, &self.dynamic_location) {
                (Some(new_static), Some(dynamic)) => new_static != dynamic,
                _ => false,
            };
            self.static_location = location;
            if conflicts {
                self.dynamic_location = None;
            }
        } else {
            self.dynamic_location = location;
        }

        previous
    }

    /// Binds `location` dynamically only when no location is set yet.
    pub fn try_bind(&mut self, location: &str) -> BindOutcome {
        if self.effective().is_some() {
            return BindOutcome::AlreadyBound;
        }
        self.dynamic_location = Some(location.to_string());
        BindOutcome::Bound
    }

    /// Returns whether a subscriber owned by `owner` may receive the record.
    ///
    /// Unbound records and owner-less subscribers always match.
    pub fn admits(&self, owner: Option<&str>) -> bool {
        location_admits(self.effective(), owner)
    }
}

/// Returns whether a record bound to `bound` may reach a subscriber owned by
/// `owner`.
pub fn location_admits(bound: Option<&str>, owner: Option<&str>) -> bool {
    match (bound, owner) {
        (Some(bound), Some(owner)) => bound == owner,
        _ => true,
    }
}
