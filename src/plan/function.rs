//! Packaging a plan as an emittable function.

use crate::native::{NativeEngine, NativeMapping};
use crate::nest::Array;
use crate::plan::builder::{BuiltPlan, Plan};
use crate::target::Target;
use crate::utils::errors::NestPlanResult;
use log::info;
use rand::Rng;

/// A plan bound to its buffer arguments under a unique symbol name.
#[derive(Debug)]
pub struct Function<'s> {
    name: String,
    args: Vec<Array>,
    public: bool,
    no_inline: bool,
    plan: Plan<'s>,
}

/// A fresh `nest_impl_<32 hex digits>` symbol.
fn unique_name() -> String {
    format!("nest_impl_{:032x}", rand::thread_rng().gen::<u128>())
}

impl<'s> Function<'s> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Array] {
        &self.args
    }

    pub fn is_public(&self) -> bool {
        self.public
    }

    pub fn no_inline(&self) -> bool {
        self.no_inline
    }

    pub fn target(&self) -> &Target {
        self.plan.target()
    }

    pub fn plan(&self) -> &Plan<'s> {
        &self.plan
    }

    /// Build the wrapped plan. Every argument must have a native buffer.
    pub fn emit<E: NativeEngine>(self, engine: &mut E, mapping: &NativeMapping) -> NestPlanResult<BuiltPlan<E::Plan>> {
        for arg in &self.args {
            mapping.buffer(arg)?;
        }
        info!("Emitting {} ({} argument(s))", self.name, self.args.len());
        self.plan.build(engine, mapping)
    }
}

impl<'s> Plan<'s> {
    /// Wrap this plan as a function taking `args`.
    pub fn into_function(self, args: Vec<Array>, public: bool, no_inline: bool) -> Function<'s> {
        Function {
            name: unique_name(),
            args,
            public,
            no_inline,
            plan: self,
        }
    }
}
