//! YAML rule and workflow definitions.
//!
//! Every document carries an `apiVersion`/`kind`/`metadata` envelope and a
//! kind-specific `spec`:
//!
//! ```yaml
//! apiVersion: v1
//! kind: Rule
//! metadata:
//!   id: session-drop
//!   name: Session drop
//! spec:
//!   workflow: session-drop-response
//!   conditionLogic: all
//!   conditions:
//!     - field: sessions
//!       operator: lt
//!       value: 20
//! ```

mod document;
mod loader;
mod seed;

pub use document::*;
pub use loader::*;
pub use seed::*;
