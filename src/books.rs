//! Built-in textbook catalog

/// A textbook the backend can answer questions from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Book {
    /// Short id used on the command line
    pub id: &'static str,
    /// Backend identifier sent to `init` and stored with chat sessions
    pub file: &'static str,
    /// Display name
    pub title: &'static str,
}

/// Every supported book
pub const CATALOG: &[Book] = &[
    Book {
        id: "class6",
        file: "NCERT6thbook.json",
        title: "Class 6 Science",
    },
    Book {
        id: "class7",
        file: "NCERT7thbook.json",
        title: "Class 7 Science",
    },
    Book {
        id: "class9",
        file: "NCERT9thbook.json",
        title: "Class 9 Science",
    },
    Book {
        id: "class10",
        file: "NCERT10thbook.json",
        title: "Class 10 Science",
    },
];

/// Look up a book by id, backend file name, or bare class number
#[must_use]
pub fn find(key: &str) -> Option<&'static Book> {
    let key = key.trim();
    CATALOG.iter().find(|book| {
        book.id.eq_ignore_ascii_case(key)
            || book.file.eq_ignore_ascii_case(key)
            || book.id.strip_prefix("class") == Some(key)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_by_any_key() {
        assert_eq!(find("class9").map(|b| b.file), Some("NCERT9thbook.json"));
        assert_eq!(find("CLASS9").map(|b| b.file), Some("NCERT9thbook.json"));
        assert_eq!(find("NCERT10thbook.json").map(|b| b.id), Some("class10"));
        assert_eq!(find(" 6 ").map(|b| b.title), Some("Class 6 Science"));
    }

    #[test]
    fn test_unknown_book() {
        assert!(find("class8").is_none());
        assert!(find("").is_none());
    }
}
