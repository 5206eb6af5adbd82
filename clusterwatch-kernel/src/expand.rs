/**
 * EXPANSION DES PLAGES D'INSTANCES
 *
 * RÔLE :
 * Transforme la notation compacte des champs `instances` en liste de noms.
 *
 * EXEMPLES :
 * - "su1-gpu[1-3]"        -> su1-gpu1, su1-gpu2, su1-gpu3
 * - "storage[01-03]-a"    -> storage01-a, storage02-a, storage03-a
 * - "a,b[1-2]"            -> a, b1, b2
 *
 * Le zéro-padding n'est appliqué que si début et fin ont le même nombre de
 * chiffres ET que le début commence par '0'. "[0-9]" n'est donc pas paddé.
 */

/// Nombre maximal de noms produits par une seule plage
pub const MAX_RANGE: u64 = 100_000;

/// Développe un champ brut (segments séparés par des virgules) dans l'ordre des segments
pub fn expand_instances(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        expand_segment(segment, &mut out);
    }
    out
}

fn expand_segment(segment: &str, out: &mut Vec<String>) {
    let Some(range) = find_range(segment) else {
        out.push(segment.to_string());
        return;
    };

    // start > end : expansion vide, pas d'inversion
    if range.start > range.end {
        return;
    }
    // plage démesurée : segment malformé, rien n'est produit
    if range.end - range.start >= MAX_RANGE {
        tracing::warn!(
            "range in {segment:?} spans {} names (max {MAX_RANGE}), segment skipped",
            u128::from(range.end - range.start) + 1
        );
        return;
    }

    let width = if range.start_digits.len() == range.end_digits.len() && range.start_digits.starts_with('0') {
        range.start_digits.len()
    } else {
        0
    };

    for i in range.start..=range.end {
        out.push(format!("{}{:0width$}{}", range.prefix, i, range.suffix, width = width));
    }
}

struct RangeToken<'a> {
    prefix: &'a str,
    suffix: &'a str,
    start_digits: &'a str,
    end_digits: &'a str,
    start: u64,
    end: u64,
}

/// Cherche le dernier `[digits-digits]` du segment (préfixe gourmand)
fn find_range(segment: &str) -> Option<RangeToken<'_>> {
    let mut search_end = segment.len();
    while let Some(open) = segment[..search_end].rfind('[') {
        if let Some(token) = parse_bracket(segment, open) {
            return Some(token);
        }
        search_end = open;
    }
    None
}

fn parse_bracket(segment: &str, open: usize) -> Option<RangeToken<'_>> {
    let body_start = open + 1;
    let close = body_start + segment[body_start..].find(']')?;
    let (start_digits, end_digits) = segment[body_start..close].split_once('-')?;

    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(start_digits) || !all_digits(end_digits) {
        return None;
    }

    Some(RangeToken {
        prefix: &segment[..open],
        suffix: &segment[close + 1..],
        start_digits,
        end_digits,
        start: start_digits.parse().ok()?,
        end: end_digits.parse().ok()?,
    })
}
