//! Comparators behind [`SortType`].
//!
//! Missing fields sort before present ones. An unscanned (`Initial`) tuple has
//! no fields, so it sorts first instead of blocking the sort.

use std::cmp::Ordering;

use playlist_types::{SortType, Tuple, basename};

use crate::entry::Entry;

/// Compare two entries under `scheme`.
pub(crate) fn compare(scheme: SortType, a: &Entry, b: &Entry) -> Ordering {
    match scheme {
        SortType::Path => compare_path(&a.filename, &b.filename),
        SortType::Filename => natural_cmp(basename(&a.filename), basename(&b.filename)),
        _ => compare_tuples(scheme, &a.tuple, &b.tuple),
    }
}

/// Compare metadata under a tuple-based `scheme`.
pub(crate) fn compare_tuples(scheme: SortType, a: &Tuple, b: &Tuple) -> Ordering {
    fn text(t: &Tuple, scheme: SortType) -> Option<&str> {
        let field = match scheme {
            SortType::Title => &t.title,
            SortType::Album => &t.album,
            SortType::Artist => &t.artist,
            SortType::AlbumArtist => &t.album_artist,
            SortType::Genre => &t.genre,
            SortType::FormattedTitle => &t.formatted_title,
            SortType::Comment => &t.comment,
            SortType::Publisher => &t.publisher,
            SortType::CatalogNum => &t.catalog_number,
            _ => return None,
        };
        field.as_deref()
    }

    fn number(t: &Tuple, scheme: SortType) -> Option<i64> {
        match scheme {
            SortType::Date => t.year.map(i64::from),
            SortType::Track => t.track.map(i64::from),
            SortType::Disc => t.disc.map(i64::from),
            SortType::Length => t.length_ms,
            _ => None,
        }
    }

    match scheme {
        SortType::Date | SortType::Track | SortType::Disc | SortType::Length => {
            number(a, scheme).cmp(&number(b, scheme))
        }
        SortType::Path | SortType::Filename => Ordering::Equal,
        _ => match (text(a, scheme), text(b, scheme)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => natural_cmp(x, y),
        },
    }
}

/// Path order where a subfolder sorts after the files of its parent folder.
fn compare_path(a: &str, b: &str) -> Ordering {
    let dir_a = a.len() - basename(a).len();
    let dir_b = b.len() - basename(b).len();
    let shared = dir_a.min(dir_b);
    if dir_a != dir_b && a.as_bytes()[..shared] == b.as_bytes()[..shared] {
        return dir_a.cmp(&dir_b);
    }
    natural_cmp(a, b)
}

/// Case-insensitive comparison that orders digit runs by value (`2` < `10`).
pub(crate) fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut xs = a.chars().peekable();
    let mut ys = b.chars().peekable();
    loop {
        match (xs.peek().copied(), ys.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let n = take_number(&mut xs);
                let m = take_number(&mut ys);
                let ord = n
                    .trim_start_matches('0')
                    .len()
                    .cmp(&m.trim_start_matches('0').len())
                    .then_with(|| n.trim_start_matches('0').cmp(m.trim_start_matches('0')));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
                xs.next();
                ys.next();
            }
        }
    }
}

fn take_number<I: Iterator<Item = char>>(it: &mut std::iter::Peekable<I>) -> String {
    let mut digits = String::new();
    while let Some(c) = it.next_if(|c| c.is_ascii_digit()) {
        digits.push(c);
    }
    digits
}
