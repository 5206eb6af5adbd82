use crate::models::DeviceModelDescriptor;
use std::collections::HashSet;

/// Extrait les check functions d'un device model, ordre de première apparition.
/// Le nom est la partie avant le premier blanc, les arguments sont ignorés.
pub fn extract_check_functions(model: &DeviceModelDescriptor) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for lines in model.check_lines() {
        for line in lines {
            let name = check_function_name(line);
            if name.is_empty() {
                continue;
            }
            if seen.insert(name) {
                out.push(name.to_string());
            }
        }
    }
    out
}

/// "gpu_temp_check 85" -> "gpu_temp_check"
pub fn check_function_name(line: &str) -> &str {
    line.split(char::is_whitespace).next().unwrap_or_default()
}
