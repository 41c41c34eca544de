//! Narrow interfaces to everything outside the engine: HTTP, browser,
//! document extraction and mail.

mod browser;
mod document;
mod extract;
mod fetch;
mod mail;

pub use browser::{BrowserDriver, BrowserLauncher, LazyBrowser, NoBrowser};
#[cfg(feature = "chromium")]
pub use browser::chromium::ChromiumLauncher;
pub use document::{DocumentExtractor, ElementExtract, HtmlExtractor};
pub(crate) use extract::display;
pub use extract::{Convert, FieldSpec, Optional, RegexSpec, SplitSpec, TextMode, ValuePipeline};
pub use fetch::{Fetcher, HttpFetcher};
pub use mail::{Attachment, LogMailer, Mail, Mailer};
