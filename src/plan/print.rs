//! Annotated loop nest listing.
//!
//! Prints the schedule as nested loops with the tags each plan operation left
//! on its indices:
//!
//! ```text
//! for i in 0..4 { // parallelized
//!   for j in 0..8 { // cache, unrolled
//!     ...
//!   }
//! }
//! ```

use crate::plan::builder::Plan;
use crate::utils::format_list;
use crate::utils::pretty::PrettyPrint;
use pretty::{DocAllocator, DocBuilder};

/// Borrowed view of a plan that renders as a loop listing.
pub struct PlanListing<'p, 's> {
    plan: &'p Plan<'s>,
}

impl<'p, 's> PlanListing<'p, 's> {
    pub fn new(plan: &'p Plan<'s>) -> Self {
        Self { plan }
    }

    fn header(&self, index: &crate::nest::SymbolicIndex) -> String {
        let schedule = self.plan.schedule();
        let extent = schedule.extent(index).unwrap_or(0);
        let mut notes: Vec<String> = Vec::new();
        if let Some(factor) = schedule.split_factor(index) {
            notes.push(format!("split {}", factor));
        }
        notes.extend(self.plan.attributes().get(index).iter().map(|a| a.to_string()));

        if notes.is_empty() {
            format!("for {} in 0..{} {{", index, extent)
        } else {
            format!("for {} in 0..{} {{ // {}", index, extent, format_list(&notes, ", "))
        }
    }
}

impl PrettyPrint for PlanListing<'_, '_> {
    fn to_doc<'a, D: DocAllocator<'a>>(&self, allocator: &'a D) -> DocBuilder<'a, D> {
        let mut doc = allocator.text("...");
        for index in self.plan.schedule().indices().iter().rev() {
            doc = allocator
                .text(self.header(index))
                .append(allocator.hardline().append(doc).nest(2))
                .append(allocator.hardline())
                .append(allocator.text("}"));
        }
        doc
    }
}

impl<'s> Plan<'s> {
    /// The loop listing as a string.
    pub fn render(&self) -> String {
        PlanListing::new(self).pretty()
    }

    /// Print the loop listing to stdout.
    pub fn print(&self) {
        println!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use crate::nest::{IterationSpace, Schedule};
    use crate::native::ParallelPolicy;
    use crate::plan::Plan;
    use crate::target::Target;

    #[test]
    fn test_render_tags() {
        let space = IterationSpace::new(&[("i", 4), ("j", 8)]);
        let sched = Schedule::new(&space);
        let mut plan = Plan::new(&sched, Target::host());
        plan.parallelize(space.index(0).unwrap(), None, ParallelPolicy::Static).unwrap();
        plan.unroll(space.index(1).unwrap()).unwrap();

        let expected = "for i in 0..4 { // parallelized\n  for j in 0..8 { // unrolled\n    ...\n  }\n}";
        assert_eq!(plan.render(), expected);
    }

    #[test]
    fn test_render_split() {
        let space = IterationSpace::new(&[("i", 64)]);
        let mut sched = Schedule::new(&space);
        sched.split(space.index(0).unwrap(), 16).unwrap();
        let plan = Plan::new(&sched, Target::host());

        let out = plan.render();
        assert!(out.starts_with("for i in 0..4 { // split 16\n  for i_in in 0..16 {"));
    }
}
