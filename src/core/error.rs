//! Error types for nodeclass

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using nodeclass's Error
pub type Result<T> = std::result::Result<T, Error>;

// BSD-style exit codes, matching sysexits.h
pub const EX_OK: i32 = 0;
pub const EX_USAGE: i32 = 64;
pub const EX_DATAERR: i32 = 65;
pub const EX_SOFTWARE: i32 = 70;
pub const EX_IOERR: i32 = 74;
pub const EX_NOPERM: i32 = 77;
pub const EX_CONFIG: i32 = 78;

/// nodeclass error types
///
/// Interpolation-family errors carry breadcrumbs (node name, context path,
/// source uri) that are filled in as the error propagates outward.
#[derive(Error, Debug)]
pub enum Error {
    // Note: `Clone` is implemented manually below; `std::io::Error`,
    // `serde_yaml::Error` and `serde_json::Error` do not implement `Clone`,
    // so the `Io`, `YamlParse` and `Json` variants are reconstructed from
    // their display text instead of cloned directly.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot read {}: permission denied", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("YAML error in {uri}: {source}")]
    YamlParse {
        uri: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("the inventory URIs must not be the same for nodes and classes: {uri}")]
    DuplicateUri { uri: String },

    #[error("the URIs for the nodes and classes inventories must not overlap, but {nodes_uri} and {classes_uri} do")]
    UriOverlap { nodes_uri: String, classes_uri: String },

    #[error("malformed document {uri}: {message}")]
    InvalidDocument { uri: String, message: String },

    #[error("node '{name}' not found under {storage}://{uri}")]
    NodeNotFound {
        storage: String,
        name: String,
        uri: String,
    },

    #[error("{storage}: definition of node '{name}' in '{uri2}' collides with definition in '{uri1}'; nodes can only be defined once per inventory")]
    DuplicateNodeName {
        storage: String,
        name: String,
        uri1: String,
        uri2: String,
    },

    #[error("invalid character {character:?} in class name '{classname}'")]
    InvalidClassname { character: char, classname: String },

    #[error("error in class mapping: {message}")]
    MappingFormat { message: String },

    #[error("class '{name}' not found under {storage}://{uri}{}", suffix("", "", .nodename))]
    ClassNotFound {
        storage: String,
        name: String,
        uri: String,
        nodename: String,
    },

    #[error("class name '{classname}' not resolvable{}", suffix("", .uri, .nodename))]
    ClassNameResolve {
        classname: String,
        uri: String,
        nodename: String,
    },

    #[error("inventory queries: {0}")]
    InvQueryClassNotFound(#[source] Box<Error>),

    #[error("inventory queries: {0}")]
    InvQueryClassNameResolve(#[source] Box<Error>),

    #[error("parse error: {message} in \"{text}\" at column {col}{}", suffix("", .uri, ""))]
    Parse {
        message: String,
        text: String,
        col: usize,
        uri: String,
    },

    #[error("expression error: {message}{}", suffix(.context, .uri, .nodename))]
    Expression {
        message: String,
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("cannot resolve ${{{reference}}}{}", suffix(.context, .uri, .nodename))]
    Resolve {
        reference: String,
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("{}", resolve_list(.0))]
    ResolveList(Vec<Error>),

    #[error("infinite recursion: ${{{reference}}}{}", suffix(.context, .uri, .nodename))]
    InfiniteRecursion {
        reference: String,
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("bad references{}: {}", suffix(.context, .uri, .nodename), .refs.join(", "))]
    BadReferences {
        refs: Vec<String>,
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("cannot merge {over} over {under}{}", suffix(.context, .uri, .nodename))]
    TypeMerge {
        over: &'static str,
        under: &'static str,
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("attempt to change constant value{}", suffix(.context, .uri, .nodename))]
    ChangedConstant {
        context: String,
        uri: String,
        nodename: String,
    },

    #[error("failed inventory query {query}{}: {source}", suffix(.context, .uri, .nodename))]
    InvQuery {
        query: String,
        context: String,
        uri: String,
        nodename: String,
        #[source]
        source: Box<Error>,
    },
}

impl Clone for Error {
    fn clone(&self) -> Self {
        use serde::de::Error as _;
        match self {
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::PermissionDenied { path } => Error::PermissionDenied { path: path.clone() },
            Error::YamlParse { uri, source } => Error::YamlParse {
                uri: uri.clone(),
                source: serde_yaml::Error::custom(source.to_string()),
            },
            Error::Json(e) => Error::Json(serde_json::Error::custom(e.to_string())),
            Error::Config { message } => Error::Config {
                message: message.clone(),
            },
            Error::DuplicateUri { uri } => Error::DuplicateUri { uri: uri.clone() },
            Error::UriOverlap {
                nodes_uri,
                classes_uri,
            } => Error::UriOverlap {
                nodes_uri: nodes_uri.clone(),
                classes_uri: classes_uri.clone(),
            },
            Error::InvalidDocument { uri, message } => Error::InvalidDocument {
                uri: uri.clone(),
                message: message.clone(),
            },
            Error::NodeNotFound { storage, name, uri } => Error::NodeNotFound {
                storage: storage.clone(),
                name: name.clone(),
                uri: uri.clone(),
            },
            Error::DuplicateNodeName {
                storage,
                name,
                uri1,
                uri2,
            } => Error::DuplicateNodeName {
                storage: storage.clone(),
                name: name.clone(),
                uri1: uri1.clone(),
                uri2: uri2.clone(),
            },
            Error::InvalidClassname {
                character,
                classname,
            } => Error::InvalidClassname {
                character: *character,
                classname: classname.clone(),
            },
            Error::MappingFormat { message } => Error::MappingFormat {
                message: message.clone(),
            },
            Error::ClassNotFound {
                storage,
                name,
                uri,
                nodename,
            } => Error::ClassNotFound {
                storage: storage.clone(),
                name: name.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::ClassNameResolve {
                classname,
                uri,
                nodename,
            } => Error::ClassNameResolve {
                classname: classname.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::InvQueryClassNotFound(source) => {
                Error::InvQueryClassNotFound(source.clone())
            }
            Error::InvQueryClassNameResolve(source) => {
                Error::InvQueryClassNameResolve(source.clone())
            }
            Error::Parse {
                message,
                text,
                col,
                uri,
            } => Error::Parse {
                message: message.clone(),
                text: text.clone(),
                col: *col,
                uri: uri.clone(),
            },
            Error::Expression {
                message,
                context,
                uri,
                nodename,
            } => Error::Expression {
                message: message.clone(),
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::Resolve {
                reference,
                context,
                uri,
                nodename,
            } => Error::Resolve {
                reference: reference.clone(),
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::ResolveList(errors) => Error::ResolveList(errors.clone()),
            Error::InfiniteRecursion {
                reference,
                context,
                uri,
                nodename,
            } => Error::InfiniteRecursion {
                reference: reference.clone(),
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::BadReferences {
                refs,
                context,
                uri,
                nodename,
            } => Error::BadReferences {
                refs: refs.clone(),
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::TypeMerge {
                over,
                under,
                context,
                uri,
                nodename,
            } => Error::TypeMerge {
                over: *over,
                under: *under,
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::ChangedConstant {
                context,
                uri,
                nodename,
            } => Error::ChangedConstant {
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
            },
            Error::InvQuery {
                query,
                context,
                uri,
                nodename,
                source,
            } => Error::InvQuery {
                query: query.clone(),
                context: context.clone(),
                uri: uri.clone(),
                nodename: nodename.clone(),
                source: source.clone(),
            },
        }
    }
}

fn suffix(context: &str, uri: &str, nodename: &str) -> String {
    let mut out = String::new();
    if !context.is_empty() {
        out.push_str(", at ");
        out.push_str(context);
    }
    if !uri.is_empty() {
        out.push_str(", in ");
        out.push_str(uri);
    }
    if !nodename.is_empty() {
        out.push_str(" (node ");
        out.push_str(nodename);
        out.push(')');
    }
    out
}

fn resolve_list(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Process exit code for this error, following sysexits.h conventions.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Io(_) | Error::NodeNotFound { .. } => EX_IOERR,
            Error::PermissionDenied { .. } => EX_NOPERM,
            Error::Config { .. } | Error::DuplicateUri { .. } | Error::UriOverlap { .. } => {
                EX_CONFIG
            }
            Error::Json(_) => EX_SOFTWARE,
            _ => EX_DATAERR,
        }
    }

    /// True for errors raised while resolving references; these are the ones
    /// collected into a group when `group_errors` is enabled.
    pub fn is_resolve_error(&self) -> bool {
        matches!(self, Error::Resolve { .. } | Error::ResolveList(_))
    }

    /// Fill in the context path breadcrumb where it is still empty.
    pub fn with_context(mut self, path: &str) -> Self {
        if let Error::Expression { context, .. }
        | Error::Resolve { context, .. }
        | Error::InfiniteRecursion { context, .. }
        | Error::BadReferences { context, .. }
        | Error::TypeMerge { context, .. }
        | Error::ChangedConstant { context, .. }
        | Error::InvQuery { context, .. } = &mut self
        {
            if context.is_empty() {
                *context = path.to_string();
            }
        }
        self
    }

    /// Fill in the source uri breadcrumb where it is still empty.
    pub fn with_uri(mut self, source_uri: &str) -> Self {
        if let Error::Parse { uri, .. }
        | Error::Expression { uri, .. }
        | Error::Resolve { uri, .. }
        | Error::InfiniteRecursion { uri, .. }
        | Error::BadReferences { uri, .. }
        | Error::TypeMerge { uri, .. }
        | Error::ChangedConstant { uri, .. }
        | Error::InvQuery { uri, .. } = &mut self
        {
            if uri.is_empty() {
                *uri = source_uri.to_string();
            }
        }
        self
    }

    /// Fill in the node name breadcrumb where it is still empty.
    pub fn with_nodename(mut self, name: &str) -> Self {
        match &mut self {
            Error::ClassNotFound { nodename, .. }
            | Error::ClassNameResolve { nodename, .. }
            | Error::Expression { nodename, .. }
            | Error::Resolve { nodename, .. }
            | Error::InfiniteRecursion { nodename, .. }
            | Error::BadReferences { nodename, .. }
            | Error::TypeMerge { nodename, .. }
            | Error::ChangedConstant { nodename, .. }
            | Error::InvQuery { nodename, .. } => {
                if nodename.is_empty() {
                    *nodename = name.to_string();
                }
            }
            Error::ResolveList(errors) => {
                let owned = std::mem::take(errors);
                *errors = owned.into_iter().map(|e| e.with_nodename(name)).collect();
            }
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_message_with_breadcrumbs() {
        let err = Error::Resolve {
            reference: "foo:bar".to_string(),
            context: String::new(),
            uri: String::new(),
            nodename: String::new(),
        }
        .with_context("greet")
        .with_uri("yaml_fs:///inv/nodes/n1.yml")
        .with_nodename("n1");
        let msg = err.to_string();
        assert!(msg.contains("${foo:bar}"));
        assert!(msg.contains("at greet"));
        assert!(msg.contains("in yaml_fs:///inv/nodes/n1.yml"));
        assert!(msg.contains("node n1"));
    }

    #[test]
    fn test_breadcrumbs_do_not_overwrite() {
        let err = Error::Resolve {
            reference: "x".to_string(),
            context: "a:b".to_string(),
            uri: String::new(),
            nodename: String::new(),
        }
        .with_context("c:d");
        match err {
            Error::Resolve { context, .. } => assert_eq!(context, "a:b"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_exit_codes() {
        let not_found = Error::NodeNotFound {
            storage: "yaml_fs".to_string(),
            name: "n1".to_string(),
            uri: "/inv/nodes".to_string(),
        };
        assert_eq!(not_found.exit_code(), EX_IOERR);
        let overlap = Error::UriOverlap {
            nodes_uri: "/inv".to_string(),
            classes_uri: "/inv/classes".to_string(),
        };
        assert_eq!(overlap.exit_code(), EX_CONFIG);
        let resolve = Error::Resolve {
            reference: "x".to_string(),
            context: String::new(),
            uri: String::new(),
            nodename: String::new(),
        };
        assert_eq!(resolve.exit_code(), EX_DATAERR);
    }

    #[test]
    fn test_grouped_errors_render_one_per_line() {
        let grouped = Error::ResolveList(vec![
            Error::Resolve {
                reference: "a".to_string(),
                context: String::new(),
                uri: String::new(),
                nodename: String::new(),
            },
            Error::Resolve {
                reference: "b".to_string(),
                context: String::new(),
                uri: String::new(),
                nodename: String::new(),
            },
        ]);
        assert_eq!(grouped.to_string().lines().count(), 2);
    }
}
