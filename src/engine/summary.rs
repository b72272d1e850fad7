//! Pass results and the process exit status derived from them.

use std::fmt;

/// Declaration category an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Users,
    Databases,
    Extensions,
    ReplicationSlots,
    Roles,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Users,
        Category::Databases,
        Category::Extensions,
        Category::ReplicationSlots,
        Category::Roles,
    ];
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Users => "users",
            Category::Databases => "databases",
            Category::Extensions => "extensions",
            Category::ReplicationSlots => "replication slots",
            Category::Roles => "roles",
        })
    }
}

/// One object that could not be brought in line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub category: Category,
    pub object: String,
    pub message: String,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}': {}", self.category, self.object, self.message)
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Default)]
pub struct PassSummary {
    /// Declarations that changed the cluster
    pub changed: usize,
    /// Declarations already in line
    pub no_change: usize,
    /// Undeclared objects removed or revoked
    pub pruned: usize,
    pub failures: Vec<Failure>,
}

impl PassSummary {
    pub fn total_changes(&self) -> usize {
        self.changed + self.pruned
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    /// Count an applied declaration.
    pub fn record(&mut self, changed: bool) {
        if changed {
            self.changed += 1;
        } else {
            self.no_change += 1;
        }
    }

    /// Count a failed object and log it.
    pub fn fail(&mut self, category: Category, object: &str, error: impl fmt::Display) {
        let failure = Failure {
            category,
            object: object.to_string(),
            message: error.to_string(),
        };
        log::error!("Failed to process {failure}");
        self.failures.push(failure);
    }

    /// Whether any object of a category failed.
    pub fn failed_in(&self, category: Category) -> bool {
        self.failures.iter().any(|f| f.category == category)
    }

    /// Failures per category, in category order, leaving out empty ones.
    pub fn failures_by_category(&self) -> Vec<(Category, usize)> {
        Category::ALL
            .iter()
            .map(|c| (*c, self.failures.iter().filter(|f| f.category == *c).count()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Process exit status for an accumulated error count.
///
/// Exit statuses are taken modulo 256, so a nonzero multiple of 256 is
/// bumped by one to keep it from reading as success.
pub fn exit_status(errors: usize) -> i32 {
    let errors = if errors > 0 && errors % 256 == 0 {
        errors + 1
    } else {
        errors
    };
    i32::try_from(errors).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_multiple_of_256() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(255), 255);
        assert_eq!(exit_status(256), 257);
        assert_eq!(exit_status(512), 513);
        assert_eq!(exit_status(257), 257);
    }

    #[test]
    fn test_record_and_fail() {
        let mut summary = PassSummary::default();
        summary.record(true);
        summary.record(false);
        summary.record(false);
        summary.pruned = 2;
        assert_eq!(summary.total_changes(), 3);
        assert_eq!(summary.no_change, 2);
        assert!(summary.is_success());

        summary.fail(Category::Users, "alice", "invalid role options");
        summary.fail(Category::Users, "bob", "directory unreachable");
        summary.fail(Category::Extensions, "shop.hstore", "not available");
        assert!(!summary.is_success());
        assert_eq!(summary.error_count(), 3);
        assert!(summary.failed_in(Category::Users));
        assert!(!summary.failed_in(Category::Roles));
        assert_eq!(
            summary.failures_by_category(),
            vec![(Category::Users, 2), (Category::Extensions, 1)]
        );
        assert_eq!(
            summary.failures[0].to_string(),
            "users 'alice': invalid role options"
        );
    }
}
