pub mod hanvon;
