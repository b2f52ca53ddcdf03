use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref COLOR_CODE: Regex = Regex::new(r"\^[0-9]").unwrap();
}

/// Remove `^<digit>` color escapes, e.g. for plain text listings.
pub fn strip_color_codes(input: &str) -> Cow<'_, str> {
    COLOR_CODE.replace_all(input, "")
}
