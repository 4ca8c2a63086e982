use serde_json::{Map, Value};
use spinta_core::{ErrorCode, Reportable};
use thiserror::Error;

use crate::token::Span;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SpynaError {
    #[error("syntax error at {}..{}: {message}", span.start, span.end)]
    Syntax { message: String, span: Span },

    #[error("invalid expression node: {0}")]
    InvalidNode(String),
}

impl SpynaError {
    pub fn span(&self) -> Option<Span> {
        match self {
            SpynaError::Syntax { span, .. } => Some(*span),
            SpynaError::InvalidNode(_) => None,
        }
    }
}

impl Reportable for SpynaError {
    fn code(&self) -> ErrorCode {
        ErrorCode::SpynaSyntaxError
    }

    fn context(&self) -> Map<String, Value> {
        let mut context = Map::new();
        if let SpynaError::Syntax { span, .. } = self {
            context.insert("offset".into(), Value::from(span.start));
        }
        context
    }
}
