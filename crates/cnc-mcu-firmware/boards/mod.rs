pub mod stm32f407;
