//! Directives: named, argument-carrying annotations attached to AST nodes.
//!
//! `#[native(lib="host")]` preceding a function means its emitted descriptor
//! is a native binding with no body. Unknown directives are accepted on any
//! node that opts in via [`supports_directive`](Directive::applies_to_unknown).

use std::collections::HashMap;

/// A single `#[name(key=value, ...)]` directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// The directive's name, e.g. `native`.
    pub name: String,
    /// Its `key = value` arguments, in source order.
    pub args: HashMap<String, String>,
}

impl Directive {
    /// Construct a directive from a name and argument map.
    pub fn new(name: impl Into<String>, args: HashMap<String, String>) -> Self {
        Directive {
            name: name.into(),
            args,
        }
    }

    /// Fetch a string-valued argument.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(|s| s.as_str())
    }
}

/// The parser pushes directives preceding a top-level item or statement onto
/// this stack and pops them once that item has been fully parsed, so nested
/// items never see an ancestor's directives.
#[derive(Debug, Clone, Default)]
pub struct DirectiveStack {
    frames: Vec<Vec<Directive>>,
}

impl DirectiveStack {
    /// An empty stack.
    pub fn new() -> Self {
        DirectiveStack { frames: Vec::new() }
    }

    /// Push a fresh frame containing the given directives.
    pub fn push(&mut self, directives: Vec<Directive>) {
        self.frames.push(directives);
    }

    /// Pop the most recently pushed frame, returning its directives.
    pub fn pop(&mut self) -> Vec<Directive> {
        self.frames.pop().unwrap_or_default()
    }

    /// The directives visible at the top of the stack right now.
    pub fn current(&self) -> &[Directive] {
        self.frames.last().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Returns whether unknown (non-`native`) directives are permitted on a node
/// kind that doesn't interpret them itself. Expressions opt in; statements
/// and most items do not, since an unrecognized directive there is more
/// likely a typo than an extension point.
pub fn supports_unknown_directive(on_expression: bool) -> bool {
    on_expression
}
