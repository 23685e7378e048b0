//! Player-facing messages in English and German.
//!
//! Messages use `%s` placeholders filled in order. A key missing from the
//! active table falls back to `en_us`; a key missing there renders as itself.

use std::collections::HashMap;
use std::fmt::{self, Display};
use tracing::{info, warn};

/// Prepended to every message sent to a player.
pub const PREFIX: &str = "[Flats] ";
pub const FALLBACK_LOCALE: &str = "en_us";

static EN_US: &[(&str, &str)] = &[
    ("help.header", "Available commands:"),
    ("help.select", "/flats select - Get the selection wand"),
    ("help.add", "/flats add <name> - Add your selection as a flat or an area of one"),
    ("help.remove", "/flats remove <name> - Delete a flat"),
    ("help.list", "/flats list - List all flats"),
    ("help.info", "/flats info - Show the flat you are standing in"),
    ("help.claim", "/flats claim - Claim the flat you are standing in"),
    ("help.unclaim", "/flats unclaim - Give up the flat you are standing in"),
    ("help.trust", "/flats trust <player> - Let a player build in your flat"),
    ("help.untrust", "/flats untrust <player> - Revoke a player's access to your flat"),
    ("help.show", "/flats show - Highlight the flats around you"),
    ("error.no_permission", "You do not have permission to do that."),
    ("error.usage", "Usage: %s"),
    ("error.player_not_found", "The player %s has never been on this server."),
    ("error.not_in_flat", "You are not standing in a flat."),
    ("error.not_your_flat", "This is not your flat."),
    ("error.nothing_selected", "You have not selected an area yet."),
    ("error.selection_too_large", "Your selection is too large."),
    ("error.flat_intersect", "Your selection overlaps an existing flat."),
    ("error.flat_intersect.details", "Flat %s at %s"),
    ("error.flat_not_exist", "This flat does not exist."),
    ("error.command_delay", "Please wait %s more second(s) before using this command again."),
    ("error.internal", "Something went wrong. Please tell an administrator."),
    ("select.success", "You received the selection wand."),
    ("selection.set", "Position %s set (%s blocks selected)."),
    ("add.success", "Flat %s was created."),
    ("add.area_added", "Added an area to flat %s."),
    ("remove.success", "Flat %s was deleted."),
    ("claim.success", "This flat is yours now."),
    ("claim.already_your_flat", "This flat already belongs to you."),
    ("claim.already_owned_by", "This flat already belongs to %s."),
    ("claim.max_claimable_flats_reached", "You cannot own more than %s flat(s)."),
    ("unclaim.success", "You gave up this flat."),
    ("trust.success", "%s is now trusted in your flat."),
    ("trust.already_trusted", "%s is already trusted in your flat."),
    ("untrust.success", "%s is no longer trusted in your flat."),
    ("untrust.not_trusted", "%s is not trusted in your flat."),
    ("info.flat", "Flat: %s"),
    ("info.owner", "Owner: %s"),
    ("info.unoccupied", "Owner: unoccupied"),
    ("info.trusted_header", "Trusted players:"),
    ("info.trusted_item", " ├ %s"),
    ("info.trusted_last", " └ %s"),
    ("info.area", "Area: %s"),
    ("list.title", "All flats:"),
    ("list.empty", "There are no flats yet."),
    ("list.areas_header", "Areas:"),
    ("list.areas_item", " ├ %s"),
    ("list.areas_last", " └ %s"),
    ("show.none", "There are no flats near you."),
    ("show.success.singular", "Showing 1 flat for %s seconds."),
    ("show.success.plural", "Showing %s flats for %s seconds."),
];

static DE_DE: &[(&str, &str)] = &[
    ("help.header", "Verfügbare Befehle:"),
    ("help.select", "/flats select - Erhalte den Auswahlstab"),
    ("help.add", "/flats add <Name> - Füge deine Auswahl als Wohnung oder Bereich hinzu"),
    ("help.remove", "/flats remove <Name> - Lösche eine Wohnung"),
    ("help.list", "/flats list - Liste alle Wohnungen auf"),
    ("help.info", "/flats info - Zeige die Wohnung, in der du stehst"),
    ("help.claim", "/flats claim - Beanspruche die Wohnung, in der du stehst"),
    ("help.unclaim", "/flats unclaim - Gib die Wohnung, in der du stehst, auf"),
    ("help.trust", "/flats trust <Spieler> - Erlaube einem Spieler, in deiner Wohnung zu bauen"),
    ("help.untrust", "/flats untrust <Spieler> - Entziehe einem Spieler den Zugang"),
    ("help.show", "/flats show - Hebe die Wohnungen in deiner Nähe hervor"),
    ("error.no_permission", "Dazu hast du keine Berechtigung."),
    ("error.usage", "Verwendung: %s"),
    ("error.player_not_found", "Der Spieler %s war noch nie auf diesem Server."),
    ("error.not_in_flat", "Du stehst in keiner Wohnung."),
    ("error.not_your_flat", "Das ist nicht deine Wohnung."),
    ("error.nothing_selected", "Du hast noch keinen Bereich ausgewählt."),
    ("error.selection_too_large", "Deine Auswahl ist zu groß."),
    ("error.flat_intersect", "Deine Auswahl überschneidet sich mit einer Wohnung."),
    ("error.flat_intersect.details", "Wohnung %s bei %s"),
    ("error.flat_not_exist", "Diese Wohnung existiert nicht."),
    ("error.command_delay", "Bitte warte noch %s Sekunde(n), bevor du diesen Befehl erneut nutzt."),
    ("select.success", "Du hast den Auswahlstab erhalten."),
    ("selection.set", "Position %s gesetzt (%s Blöcke ausgewählt)."),
    ("add.success", "Die Wohnung %s wurde erstellt."),
    ("add.area_added", "Der Wohnung %s wurde ein Bereich hinzugefügt."),
    ("remove.success", "Die Wohnung %s wurde gelöscht."),
    ("claim.success", "Diese Wohnung gehört jetzt dir."),
    ("claim.already_your_flat", "Diese Wohnung gehört bereits dir."),
    ("claim.already_owned_by", "Diese Wohnung gehört bereits %s."),
    ("claim.max_claimable_flats_reached", "Du kannst nicht mehr als %s Wohnung(en) besitzen."),
    ("unclaim.success", "Du hast diese Wohnung aufgegeben."),
    ("trust.success", "%s darf jetzt in deiner Wohnung bauen."),
    ("trust.already_trusted", "%s darf bereits in deiner Wohnung bauen."),
    ("untrust.success", "%s darf nicht mehr in deiner Wohnung bauen."),
    ("untrust.not_trusted", "%s hat keinen Zugang zu deiner Wohnung."),
    ("info.flat", "Wohnung: %s"),
    ("info.owner", "Besitzer: %s"),
    ("info.unoccupied", "Besitzer: unbewohnt"),
    ("info.trusted_header", "Vertraute Spieler:"),
    ("info.area", "Bereich: %s"),
    ("list.title", "Alle Wohnungen:"),
    ("list.empty", "Es gibt noch keine Wohnungen."),
    ("list.areas_header", "Bereiche:"),
    ("show.none", "In deiner Nähe gibt es keine Wohnungen."),
    ("show.success.singular", "1 Wohnung wird für %s Sekunden angezeigt."),
    ("show.success.plural", "%s Wohnungen werden für %s Sekunden angezeigt."),
];

fn table(locale: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match locale.to_ascii_lowercase().replace('-', "_").as_str() {
        "en_us" => Some(EN_US),
        "de_de" => Some(DE_DE),
        _ => None,
    }
}

/// Fills `%s` placeholders in order; surplus placeholders stay as written.
fn format_message(template: &str, args: &[&dyn Display]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut rest = template;
    while let Some(at) = rest.find("%s") {
        out.push_str(&rest[..at]);
        match args.next() {
            Some(arg) => out.push_str(&arg.to_string()),
            None => out.push_str("%s"),
        }
        rest = &rest[at + 2..];
    }
    out.push_str(rest);
    out
}

/// The active translation table plus the English fallback.
#[derive(Clone)]
pub struct I18n {
    locale: String,
    active: HashMap<&'static str, &'static str>,
    fallback: HashMap<&'static str, &'static str>,
}

impl fmt::Debug for I18n {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I18n").field("locale", &self.locale).finish_non_exhaustive()
    }
}

impl Default for I18n {
    fn default() -> Self {
        Self::load(FALLBACK_LOCALE)
    }
}

impl I18n {
    /// Loads `locale`, falling back to English for unknown locales.
    pub fn load(locale: &str) -> Self {
        let fallback: HashMap<_, _> = EN_US.iter().copied().collect();
        let (locale, active) = match table(locale) {
            Some(entries) => {
                info!("Loaded translation {}", locale);
                (locale.to_string(), entries.iter().copied().collect())
            }
            None => {
                warn!("⚠️ Translation not found for locale: {}, using {}", locale, FALLBACK_LOCALE);
                (FALLBACK_LOCALE.to_string(), fallback.clone())
            }
        };
        Self {
            locale,
            active,
            fallback,
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// The translated message, or `key` itself when no table knows it.
    pub fn translate(&self, key: &str, args: &[&dyn Display]) -> String {
        match self.active.get(key).or_else(|| self.fallback.get(key)) {
            Some(template) => format_message(template, args),
            None => key.to_string(),
        }
    }

    /// [`I18n::translate`] with the chat prefix.
    pub fn message(&self, key: &str, args: &[&dyn Display]) -> String {
        format!("{}{}", PREFIX, self.translate(key, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_fill_in_order() {
        let i18n = I18n::load("en_us");
        assert_eq!(
            i18n.translate("show.success.plural", &[&3, &10]),
            "Showing 3 flats for 10 seconds."
        );
        assert_eq!(i18n.message("add.success", &[&"a1"]), "[Flats] Flat a1 was created.");
        assert_eq!(format_message("%s and %s", &[&"one"]), "one and %s");
    }

    #[test]
    fn german_falls_back_to_english_per_key() {
        let i18n = I18n::load("de_DE");
        assert_eq!(i18n.locale(), "de_DE");
        assert_eq!(i18n.translate("claim.success", &[]), "Diese Wohnung gehört jetzt dir.");
        assert_eq!(i18n.translate("info.trusted_last", &[&"Bob"]), " └ Bob");
    }

    #[test]
    fn unknown_locale_and_unknown_key() {
        let i18n = I18n::load("xx_yy");
        assert_eq!(i18n.locale(), FALLBACK_LOCALE);
        assert_eq!(i18n.translate("no.such.key", &[]), "no.such.key");
    }

    #[test]
    fn both_tables_use_the_same_placeholders() {
        for (key, german) in DE_DE {
            let english = EN_US.iter().find(|(k, _)| k == key).map(|(_, v)| *v);
            let english = english.unwrap_or_else(|| panic!("{key} missing from en_us"));
            assert_eq!(english.matches("%s").count(), german.matches("%s").count(), "{key}");
        }
    }
}
