//! CSS class list builder

use std::rc::Rc;

use smallvec::SmallVec;

use crate::error::{ComponentError, Result};

/// One argument to [`classes`]
#[derive(Clone)]
pub enum ClassArg<'a> {
    /// Space-separated class names
    Names(&'a str),
    /// Several space-separated strings
    List(Vec<&'a str>),
    /// Names included when their condition holds
    When(Vec<(&'a str, Condition)>),
}

#[derive(Clone)]
pub enum Condition {
    Flag(bool),
    Check(Rc<dyn Fn() -> bool>),
}

impl Condition {
    fn holds(&self) -> bool {
        match self {
            Condition::Flag(flag) => *flag,
            Condition::Check(check) => check(),
        }
    }
}

impl From<bool> for Condition {
    fn from(flag: bool) -> Self {
        Condition::Flag(flag)
    }
}

impl<'a> From<&'a str> for ClassArg<'a> {
    fn from(names: &'a str) -> Self {
        ClassArg::Names(names)
    }
}

fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn push_name<'a>(out: &mut SmallVec<[&'a str; 8]>, name: &'a str) -> Result<()> {
    if !is_valid_class_name(name) {
        return Err(ComponentError::InvalidClassName(name.to_string()));
    }
    if !out.contains(&name) {
        out.push(name);
    }
    Ok(())
}

fn push_names<'a>(out: &mut SmallVec<[&'a str; 8]>, names: &'a str) -> Result<()> {
    names
        .split_whitespace()
        .try_for_each(|name| push_name(out, name))
}

/// Build a space-separated class string, validating every name and dropping
/// duplicates. Conditional names are included only when their condition
/// holds; names whose condition fails are not validated.
pub fn classes(args: &[ClassArg<'_>]) -> Result<String> {
    let mut out: SmallVec<[&str; 8]> = SmallVec::new();
    for arg in args {
        match arg {
            ClassArg::Names(names) => push_names(&mut out, names)?,
            ClassArg::List(list) => {
                for names in list {
                    push_names(&mut out, names)?;
                }
            }
            ClassArg::When(entries) => {
                for (name, condition) in entries {
                    if condition.holds() {
                        push_name(&mut out, name.trim())?;
                    }
                }
            }
        }
    }
    Ok(out.join(" "))
}
