//! News-article threading: the JWZ algorithm over `Message-Id` /
//! `References` headers, producing a forest of conversation trees with
//! placeholder nodes for referenced-but-unseen messages.

pub mod article;
pub mod subject;
pub mod threader;

pub use article::Article;
pub use subject::{simplify_subject, subject_is_reply};
pub use threader::{ThreadNode, Threadable, thread};
