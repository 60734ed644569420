use crate::page::{Pageable, Sort};
use crate::value::Value;

/// Call-site arguments of a repository operation.
///
/// Positional values bind to placeholders in declaration order; a
/// [`Pageable`] or [`Sort`] rides alongside, the way a trailing paging
/// parameter would.
///
/// ```ignore
/// let args = args!["member1", 10].with_pageable(Pageable::of(0, 3));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    values: Vec<Value>,
    pageable: Option<Pageable>,
    sort: Option<Sort>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn with_pageable(mut self, pageable: Pageable) -> Self {
        self.pageable = Some(pageable);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn pageable(&self) -> Option<&Pageable> {
        self.pageable.as_ref()
    }

    pub fn sort(&self) -> Option<&Sort> {
        self.sort.as_ref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Build [`Args`] from a list of values.
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::Args::new()$(.arg($value))+
    };
}
