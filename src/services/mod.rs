pub mod polling_service;
pub mod storage_service;
pub mod telegram_service;
