//! Utility functions for common operations.
//!
//! Currently this is text processing only: converting stored HTML article
//! bodies into plain text suitable for speech synthesis.
//!
//! # Examples
//!
//! ```
//! use verso::util::plain_text_of_html;
//!
//! let text = plain_text_of_html("<p>Fish &amp; chips</p>");
//! assert_eq!(text, "Fish & chips");
//! ```

mod text;

pub use text::plain_text_of_html;
