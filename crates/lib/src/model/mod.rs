//! Resource model: templates, stacks, locations, mappings and references.

mod location;
mod reference;
mod stack;
mod template;

pub use location::{ApiLocation, ApiResourceMapping, ResourceLocation, ResourceMapping, TypedMapping, parse_location_string};
pub use reference::{ReferenceTarget, ResourceReference, map_sub_variables};
pub use stack::{Environment, Stack, StackSet, StackSetError};
pub use template::{Export, Output, Resource, Template, TemplateError};
