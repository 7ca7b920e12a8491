//! Offset planning for paginated fetches.

/// Page offsets derived from an advisory row count.
///
/// The count only sizes the plan; a page returning fewer rows than requested
/// terminates the fetch early regardless of how many offsets remain.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    total_rows: u64,
    page_size: u64,
    offsets: Vec<u64>,
}

impl FetchPlan {
    /// Plan offsets `0, page_size, 2*page_size, ...` strictly below `total_rows`.
    pub fn new(total_rows: u64, page_size: u64) -> Self {
        let page_size = page_size.max(1);
        let offsets = (0..total_rows).step_by(page_size as usize).collect();
        Self {
            total_rows,
            page_size,
            offsets,
        }
    }

    /// Planned page offsets in ascending order.
    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Number of planned pages.
    pub fn page_count(&self) -> usize {
        self.offsets.len()
    }

    /// Rows requested per page.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// The advisory total the plan was sized from.
    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Whether there is nothing to fetch.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_offsets() {
        let plan = FetchPlan::new(120_000, 50_000);
        assert_eq!(plan.offsets(), &[0, 50_000, 100_000]);
        assert_eq!(plan.page_count(), 3);
    }

    #[test]
    fn test_plan_exact_multiple() {
        let plan = FetchPlan::new(100_000, 50_000);
        assert_eq!(plan.offsets(), &[0, 50_000]);
    }

    #[test]
    fn test_plan_single_partial_page() {
        let plan = FetchPlan::new(10, 50_000);
        assert_eq!(plan.offsets(), &[0]);
    }

    #[test]
    fn test_empty_plan() {
        let plan = FetchPlan::new(0, 50_000);
        assert!(plan.is_empty());
        assert_eq!(plan.page_count(), 0);
    }
}
