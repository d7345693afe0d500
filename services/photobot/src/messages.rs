//! User-facing strings in Italian and English.

/// Supported reply languages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    It,
    En,
}

impl Locale {
    /// Pick a locale from a Telegram `language_code`, falling back to `default`
    pub fn from_language_code(code: Option<&str>, default: Locale) -> Locale {
        match code.map(|c| c.to_lowercase()) {
            Some(c) if c.starts_with("it") => Locale::It,
            Some(c) if c.starts_with("en") => Locale::En,
            _ => default,
        }
    }

    /// Parse a configured language name; unknown values fall back to Italian
    pub fn from_config(value: &str) -> Locale {
        Self::from_language_code(Some(value), Locale::It)
    }
}

pub fn start(locale: Locale) -> String {
    match locale {
        Locale::It => "Ciao, inviami un'immagine!".to_string(),
        Locale::En => "Hi, send me a picture!".to_string(),
    }
}

pub fn help(locale: Locale, literal_marker: &str) -> String {
    match locale {
        Locale::It => format!(
            "Ciao, mi presento, sono Photo Chatbot! Il mio compito è di memorizzare le immagini \
             inviate dagli utenti e di recuperarle tramite la loro descrizione.\n\n\
             Inviami un'immagine (anche con una didascalia) per salvarla.\n\
             /cerca <parole> - trova la prima immagine corrispondente\n\
             /cercatutte <parole> - trova tutte le immagini corrispondenti\n\
             /elimina - elimina le immagini dell'ultima ricerca\n\
             /conta - quante immagini hai salvato\n\n\
             Inizia la ricerca con {marker} per cercare il testo esatto, senza traduzione.",
            marker = literal_marker
        ),
        Locale::En => format!(
            "Hi, I'm Photo Chatbot! I store the pictures you send me and find them again \
             from their description.\n\n\
             Send me a picture (optionally with a caption) to save it.\n\
             /search <words> - find the first matching picture\n\
             /searchall <words> - find every matching picture\n\
             /delete - delete the pictures from your last search\n\
             /count - how many pictures you have saved\n\n\
             Start a search with {marker} to match the exact text, without translation.",
            marker = literal_marker
        ),
    }
}

pub fn help_button(locale: Locale) -> &'static str {
    match locale {
        Locale::It => "Aiuto",
        Locale::En => "Help",
    }
}

pub fn photo_received(locale: Locale, first_name: &str) -> String {
    match locale {
        Locale::It => format!("Immagine ricevuta! Grazie, {}.", first_name),
        Locale::En => format!("Picture received! Thanks, {}.", first_name),
    }
}

pub fn photo_saved(locale: Locale, labels: &str) -> String {
    if labels.is_empty() {
        return match locale {
            Locale::It => "Immagine salvata, ma non ho trovato etichette.".to_string(),
            Locale::En => "Picture saved, but no labels were found.".to_string(),
        };
    }

    match locale {
        Locale::It => format!("Immagine salvata con le etichette: {}", labels),
        Locale::En => format!("Picture saved with labels: {}", labels),
    }
}

pub fn batch_summary(locale: Locale, count: u32) -> String {
    match (locale, count) {
        (Locale::It, 1) => "1 immagine salvata.".to_string(),
        (Locale::It, n) => format!("{} immagini salvate.", n),
        (Locale::En, 1) => "1 picture saved.".to_string(),
        (Locale::En, n) => format!("{} pictures saved.", n),
    }
}

pub fn not_found(locale: Locale, query: &str) -> String {
    match locale {
        Locale::It => format!("Nessuna immagine trovata per \"{}\".", query),
        Locale::En => format!("No pictures found for \"{}\".", query),
    }
}

pub fn found(locale: Locale, count: usize) -> String {
    match (locale, count) {
        (Locale::It, 1) => "Ho trovato 1 immagine.".to_string(),
        (Locale::It, n) => format!("Ho trovato {} immagini.", n),
        (Locale::En, 1) => "Found 1 picture.".to_string(),
        (Locale::En, n) => format!("Found {} pictures.", n),
    }
}

pub fn results_truncated(locale: Locale, sent: usize) -> String {
    match locale {
        Locale::It => format!("Ti mando le prime {}.", sent),
        Locale::En => format!("Sending the first {}.", sent),
    }
}

pub fn synonym_used(locale: Locale, synonym: &str) -> String {
    match locale {
        Locale::It => format!("Risultati per il sinonimo \"{}\".", synonym),
        Locale::En => format!("Results for the synonym \"{}\".", synonym),
    }
}

pub fn deleted(locale: Locale, count: usize) -> String {
    match (locale, count) {
        (Locale::It, 1) => "1 immagine eliminata.".to_string(),
        (Locale::It, n) => format!("{} immagini eliminate.", n),
        (Locale::En, 1) => "1 picture deleted.".to_string(),
        (Locale::En, n) => format!("{} pictures deleted.", n),
    }
}

pub fn nothing_to_delete(locale: Locale) -> String {
    match locale {
        Locale::It => "Non c'è nessuna ricerca recente da eliminare.".to_string(),
        Locale::En => "There is no recent search to delete.".to_string(),
    }
}

pub fn image_count(locale: Locale, count: usize) -> String {
    match locale {
        Locale::It => format!("Hai salvato {} immagini.", count),
        Locale::En => format!("You have saved {} pictures.", count),
    }
}

pub fn search_usage(locale: Locale) -> String {
    match locale {
        Locale::It => "Scrivi cosa cercare, ad esempio: /cerca gatto".to_string(),
        Locale::En => "Tell me what to look for, for example: /search cat".to_string(),
    }
}

pub fn unknown_command(locale: Locale) -> String {
    match locale {
        Locale::It => "Comando sconosciuto. Usa /aiuto per la lista dei comandi.".to_string(),
        Locale::En => "Unknown command. Use /help to list the commands.".to_string(),
    }
}

pub fn failure(locale: Locale) -> String {
    match locale {
        Locale::It => "Si è verificato un errore, riprova più tardi.".to_string(),
        Locale::En => "Something went wrong, please try again later.".to_string(),
    }
}
