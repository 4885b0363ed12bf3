//! Error types shared by every stage of the compile-and-execute pipeline.

use crate::source::SourceLocation;
use thiserror::Error;

/// Errors produced by the lexer, parser, type checker, resolver, macro
/// expander, code generator, instruction emitter and interpreter.
///
/// Every compile-time variant carries a [`SourceLocation`]; runtime errors
/// carry only a descriptive message, matching the fail-fast contract: no
/// error is retried or recovered, and a message is all a caller can act on.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // ---- Lexical --------------------------------------------------------
    /// An unexpected character was encountered while scanning.
    #[error("{location}: unexpected character '{ch}'")]
    UnexpectedCharacter {
        /// Source location of the offending character.
        location: SourceLocation,
        /// The character itself.
        ch: char,
    },

    /// A string literal was not closed before end of line or input.
    #[error("{location}: unterminated string literal")]
    UnterminatedString {
        /// Source location where the string literal started.
        location: SourceLocation,
    },

    /// A numeric or string literal was followed by an illegal alphabetic suffix.
    #[error("{location}: invalid literal suffix")]
    InvalidSuffix {
        /// Source location of the literal.
        location: SourceLocation,
    },

    /// An unknown or malformed escape sequence appeared inside a string.
    #[error("{location}: invalid escape sequence")]
    InvalidEscape {
        /// Source location of the escape sequence.
        location: SourceLocation,
    },

    // ---- Syntactic --------------------------------------------------------
    /// The parser found a token where it did not expect one.
    #[error("{location}: unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        /// Source location of the offending token.
        location: SourceLocation,
        /// Human readable description of what was expected.
        expected: String,
        /// Human readable description of what was found.
        found: String,
    },

    /// A closing delimiter was never found.
    #[error("{location}: missing delimiter: expected {expected}")]
    MissingDelimiter {
        /// Source location where the parser gave up.
        location: SourceLocation,
        /// The delimiter that was expected.
        expected: String,
    },

    /// A block was opened but never closed.
    #[error("{location}: unterminated block")]
    UnterminatedBlock {
        /// Source location of the opening brace.
        location: SourceLocation,
    },

    // ---- Semantic / type --------------------------------------------------
    /// A name was referenced that is not defined in any visible scope.
    #[error("{location}: unknown name '{name}'")]
    UnknownName {
        /// Source location of the reference.
        location: SourceLocation,
        /// The unresolved name.
        name: String,
    },

    /// A name was declared twice in the same scope.
    #[error("{location}: duplicate definition of '{name}'")]
    DuplicateDefinition {
        /// Source location of the duplicate declaration.
        location: SourceLocation,
        /// The duplicated name.
        name: String,
    },

    /// An operator or assignment was used between incompatible types.
    #[error("{location}: type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Source location of the mismatched expression.
        location: SourceLocation,
        /// Expected type name.
        expected: String,
        /// Actual type name.
        found: String,
    },

    /// A call site did not supply the right number of arguments.
    #[error("{location}: wrong argument count for '{name}': expected {expected}, found {found}")]
    WrongArgumentCount {
        /// Source location of the call.
        location: SourceLocation,
        /// Name of the called function or macro.
        name: String,
        /// Expected argument count.
        expected: usize,
        /// Supplied argument count.
        found: usize,
    },

    /// An `as` cast was attempted between types that do not support it.
    #[error("{location}: invalid cast from {from} to {to}")]
    InvalidCast {
        /// Source location of the cast expression.
        location: SourceLocation,
        /// Source type name.
        from: String,
        /// Target type name.
        to: String,
    },

    /// `return` appeared outside of any function body.
    #[error("{location}: return outside of function")]
    ReturnOutsideFunction {
        /// Source location of the `return` statement.
        location: SourceLocation,
    },

    /// `break` or `continue` appeared outside of any loop.
    #[error("{location}: '{keyword}' outside of loop")]
    LoopControlOutsideLoop {
        /// Source location of the statement.
        location: SourceLocation,
        /// Either `break` or `continue`.
        keyword: String,
    },

    /// Importing a module created a cycle.
    #[error("recursive import detected for module '{name}'")]
    RecursiveImport {
        /// Name of the module that closes the cycle.
        name: String,
    },

    /// `null` was assigned to a non-reference type.
    #[error("{location}: cannot assign null to non-reference type {type_name}")]
    NullAssignedToValueType {
        /// Source location of the assignment.
        location: SourceLocation,
        /// The offending type name.
        type_name: String,
    },

    /// A type name never resolved to a known type after a full compile pass.
    #[error("{location}: unresolved type '{name}'")]
    UnresolvedType {
        /// Source location that referenced the type.
        location: SourceLocation,
        /// The unresolved type name.
        name: String,
    },

    // ---- Codegen ------------------------------------------------------
    /// Codegen attempted to emit into a basic block that is not the current
    /// insertion point, or no insertion point is set.
    #[error("invalid insertion point: {reason}")]
    InvalidInsertionPoint {
        /// Description of the inconsistency.
        reason: String,
    },

    /// A basic block was finished without exactly one terminator.
    #[error("malformed basic block '{label}': {reason}")]
    MalformedBlock {
        /// Label of the offending block.
        label: String,
        /// Description of the inconsistency.
        reason: String,
    },

    /// A block marked unreachable was referenced from a branch.
    #[error("unreachable block '{label}' used as a branch target")]
    UnreachableBlockUsed {
        /// Label of the offending block.
        label: String,
    },

    // ---- Emitter / module -------------------------------------------------
    /// A reference to an import or export could not be resolved while emitting.
    #[error("missing symbol in import table: {name}")]
    MissingSymbol {
        /// The unresolved symbol name.
        name: String,
    },

    /// A table or buffer grew beyond the format's representable range.
    #[error("size overflow while emitting module: {reason}")]
    SizeOverflow {
        /// Description of the overflow.
        reason: String,
    },

    // ---- Serialization ------------------------------------------------
    /// A tagged union carried a tag byte outside its valid range.
    #[error("serialization error: invalid tag {tag} for {context}")]
    InvalidTag {
        /// The offending tag byte.
        tag: u8,
        /// What was being decoded.
        context: String,
    },

    /// The byte stream ended before a value could be fully decoded.
    #[error("serialization error: truncated stream while reading {context}")]
    TruncatedStream {
        /// What was being decoded.
        context: String,
    },

    /// The module's magic tag did not match `slc2`.
    #[error("serialization error: bad module magic")]
    BadMagic,

    // ---- Runtime / interpreter ------------------------------------------
    /// The operand stack over- or under-flowed.
    #[error("runtime error: operand stack {direction}")]
    StackOverflow {
        /// Either "overflow" or "underflow".
        direction: &'static str,
    },

    /// Integer division or modulo by zero.
    #[error("runtime error: division by zero")]
    DivisionByZero,

    /// A null reference was dereferenced.
    #[error("runtime error: null reference dereferenced")]
    NullDereference,

    /// An array index fell outside `[0, length)`.
    #[error("runtime error: array index {index} out of bounds (length {length})")]
    ArrayBoundsViolation {
        /// The offending index.
        index: i32,
        /// The array's length.
        length: i32,
    },

    /// `checkcast` failed: the dynamic type did not match.
    #[error("runtime error: checkcast failed: value is not of type {expected}")]
    CheckcastFailed {
        /// The type the cast demanded.
        expected: String,
    },

    /// A native function was invoked but none is registered under that name.
    #[error("runtime error: missing native function '{name}'")]
    MissingNativeFunction {
        /// The unresolved native function name.
        name: String,
    },

    /// The garbage collector detected an internal inconsistency.
    #[error("runtime error: GC invariant violation: {reason}")]
    GcInvariantViolation {
        /// Description of the inconsistency.
        reason: String,
    },

    /// Catch-all for interpreter faults that don't fit a more specific kind,
    /// e.g. an opcode/category mismatch at execution time.
    #[error("runtime error: {0}")]
    RuntimeFault(String),
}

impl Error {
    /// Build a [`Error::RuntimeFault`] from a formatted message.
    pub fn fault(msg: impl Into<String>) -> Self {
        Error::RuntimeFault(msg.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
