//! Prompts shared by the extraction stage and the parser.
//!
//! The output contract is pinned here: one JSON object whose `data` array
//! holds `{"Nom", "Catégorie", "Prix"}` entries. [`crate::tracker::parser`]
//! accepts nothing else.

/// Key of the record array in the response object.
pub const DATA_KEY: &str = "data";
/// Record field holding the resource name.
pub const NAME_FIELD: &str = "Nom";
/// Record field holding the category.
pub const CATEGORY_FIELD: &str = "Catégorie";
/// Record field holding the price.
pub const PRICE_FIELD: &str = "Prix";

macro_rules! output_contract {
    () => {
        "Chaque ressource possède les attributs suivants : Nom, Catégorie \
         (identique pour toutes les ressources, déductible du texte), Prix \
         (nombre entier, sans symbole ni caractère parasite après le prix \
         comme €, * ou 4€).\n\n\
         Règles :\n\
         - Ignorez les informations inutiles ou redondantes.\n\
         - Une entrée par ressource.\n\
         - Si un prix est suivi de caractères inutiles, ignorez-les.\n\n\
         Répondez uniquement avec un objet JSON de la forme :\n\
         {\"data\": [{\"Nom\": \"Alliage Ivre\", \"Catégorie\": \"Alliage\", \"Prix\": 700361}, \
         {\"Nom\": \"Ardonite\", \"Catégorie\": \"Alliage\", \"Prix\": 21449}, \
         {\"Nom\": \"Aluminite\", \"Catégorie\": \"Alliage\", \"Prix\": 270}]}"
    };
}

/// System directive sent alongside an image.
pub const JSON_ONLY_SYSTEM: &str = "You are a JSON-only response bot. Always respond with a single \
     valid JSON object, without any additional text or explanation.";

/// Task prompt for a screenshot.
pub const IMAGE_PROMPT: &str = concat!(
    "Voici une image contenant des informations sur des ressources. ",
    output_contract!()
);

/// System directive for text input; the text itself is the user message.
pub const TEXT_PROMPT: &str = concat!(
    "Le message de l'utilisateur est le texte brut extrait d'une capture d'écran \
     listant des ressources et leurs prix. ",
    output_contract!()
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_example_is_valid_json() {
        let start = IMAGE_PROMPT.find("{\"data\"").unwrap();
        let example: serde_json::Value = serde_json::from_str(&IMAGE_PROMPT[start..]).unwrap();
        let first = &example[DATA_KEY][0];
        assert_eq!(first[NAME_FIELD], "Alliage Ivre");
        assert_eq!(first[CATEGORY_FIELD], "Alliage");
        assert_eq!(first[PRICE_FIELD], 700_361);
    }

    #[test]
    fn test_both_prompts_share_the_contract() {
        let tail = |p: &str| p[p.find("Chaque ressource").unwrap()..].to_string();
        assert_eq!(tail(IMAGE_PROMPT), tail(TEXT_PROMPT));
    }
}
