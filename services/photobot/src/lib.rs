//! Photobot
//!
//! Telegram bot that stores the pictures users send it and finds them again
//! from a description. Each picture is labelled by an image-recognition
//! service and written to object storage together with its labels; searches
//! translate the query, match it against every stored label set of the user
//! and send back the matching pictures.
//!
//! ## Features
//!
//! - **Automatic Labelling**: labels, localized objects and recognised text
//!   from the vision service, merged with the words of the caption
//! - **Object Store as Database**: one object per picture under
//!   `{user_id}/{photo_id}.jpg`, labels kept in the object metadata
//! - **Fuzzy Search**: substring or edit-distance matching, with synonym
//!   fallback and a literal marker that skips translation
//! - **Batched Confirmations**: a single "N pictures saved" reply per burst
//!   of uploads
//!
//! ## Architecture
//!
//! ```text
//! Telegram Bot API                                     Object Store
//! ┌──────────────┐     ┌──────────────┐               ┌──────────────┐
//! │ getUpdates   │────▶│ Update       │               │ {user_id}/   │
//! └──────────────┘     │ Poller       │               │  {photo}.jpg │
//!        ▲             └──────────────┘               │  + labels    │
//!        │                    │                       └──────────────┘
//!        │                    ▼                          ▲       ▲
//!        │             ┌──────────────┐  photo   ┌──────────────┐  │
//!        │             │ Bot          │─────────▶│ Photo        │  │
//!        │             │ Handler      │          │ Ingestor     │  │
//!        │             └──────────────┘          └──────────────┘  │
//!        │               │        │ query               │          │
//!        │               │        ▼                     ▼          │
//!        │               │  ┌──────────────┐    ┌──────────────┐   │
//!        │               │  │ Search       │    │ Vision /     │   │
//!        │               │  │ Service      │───▶│ Translate /  │   │
//!        │               │  └──────────────┘    │ Synonyms     │   │
//!        │               ▼         │            └──────────────┘   │
//!        │        ┌──────────────┐ └───────────────────────────────┘
//!        └────────│ Batch        │
//!                 │ Notifier     │◀── Session Store
//!                 └──────────────┘
//! ```

pub mod api;
pub mod batch;
pub mod config;
pub mod handlers;
pub mod ingest;
pub mod labels;
pub mod matcher;
pub mod messages;
pub mod object_store;
pub mod poller;
pub mod search;
pub mod session;
pub mod synonyms;
pub mod telegram;
pub mod translate;
pub mod vision;

pub use api::{start_api_server, AppState};
pub use batch::BatchNotifier;
pub use config::Config;
pub use handlers::{BotHandler, Command, HandlerSettings};
pub use ingest::{PhotoIngestor, StoredImage};
pub use labels::LabelSet;
pub use matcher::{QueryMatcher, QueryMatcherBuilder, SearchMode};
pub use messages::Locale;
pub use object_store::{build_image_store, ImageStore, MemoryImageStore, S3ImageStore};
pub use poller::{PollerSettings, UpdatePoller, UpdateSource};
pub use search::{SearchError, SearchOutcome, SearchService, SearchSettings};
pub use session::SessionStore;
pub use synonyms::{DatamuseClient, SynonymProvider};
pub use telegram::{ChatTransport, TelegramClient};
pub use translate::{GoogleTranslateClient, Translator};
pub use vision::{GoogleVisionClient, LabelDetector};
