//! echoform is a comment-directive preprocessor.
//! It reads `var` declarations embedded in a file's own comment syntax,
//! resolves them from files, URLs and modules, and regenerates the `echo`
//! regions of the file from expressions over those variables.

/// Built-in variables: literals, coercions, helper packs and the process snapshot
pub mod builtins;

/// Command-line interface module for the echoform binary
pub mod cli;

/// Options derivation for source files
/// Merges defaults, caller options and the in-file `.options` statement
pub mod config;

/// Common constants used throughout echoform
pub mod constants;

/// Error types and handling for echoform
pub mod error;

/// External collaborators: file system, network, modules, hashing
pub mod host;

/// Resource loading for `var` statements
/// Supports text, json, list, stat, pack and get var types
pub mod loader;

/// Logger setup for the binary
pub mod logger;

/// Directive and expression syntax
pub mod parser;

/// Core processing orchestration
/// Combines all components into one pass over a source file
pub mod processor;

/// Expression pipeline evaluation
pub mod renderer;

/// Template values and the variable store
pub mod value;
