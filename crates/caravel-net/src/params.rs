//! Client startup parameters, published as `<param name="..." value="...">`
//! pairs on each world's parameter page.

use std::collections::HashMap;

use caravel_core::world;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::download::{self, DownloadError};

static PARAMETER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<param name="(.*?)" value="(.*?)">"#).expect("parameter pattern"));

/// Extracts every parameter pair from the page markup.
pub fn parse_parameters(page: &str) -> HashMap<String, String> {
    PARAMETER_PATTERN
        .captures_iter(page)
        .map(|capture| (capture[1].to_string(), capture[2].to_string()))
        .collect()
}

/// Fetches and parses the parameter page of the given world.
pub fn fetch_parameters(world: u32) -> Result<HashMap<String, String>, DownloadError> {
    let page = download::fetch_text(&world::parameter_page_url(world))?;
    Ok(parse_parameters(&page))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_every_pair_in_the_page() {
        let page = concat!(
            "<html><body>\n",
            "<param name=\"server\" value=\"world3\">\n",
            "<param name=\"token\" value=\"a-b_c.d\">\n",
            "junk between tags\n",
            "<param name=\"mode\" value=\"live\">\n",
            "</body></html>",
        );
        let parameters = parse_parameters(page);
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters["server"], "world3");
        assert_eq!(parameters["token"], "a-b_c.d");
        assert_eq!(parameters["mode"], "live");
    }

    #[test]
    fn malformed_tags_are_ignored() {
        let page = "<param name=\"incomplete\"><param value=\"orphan\">";
        assert!(parse_parameters(page).is_empty());
    }

    #[test]
    fn empty_page_yields_no_parameters() {
        assert!(parse_parameters("").is_empty());
    }
}
