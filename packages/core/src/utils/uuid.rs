// UUID утилиты

pub fn generate_v4() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Ссылка на ключ элемента в коротко живущем хранилище
pub fn item_key_ref() -> String {
    format!("ik:{}", generate_v4())
}
