use crate::{
    command::Command, command_bus::CommandBus, command_handler::CommandHandler,
    context::AppContext, error::AppError,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::any::{Any, TypeId, type_name};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxAnySend = Box<dyn Any + Send>;

type CmdHandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxAnySend, AppError>> + Send + 'a>>;

type CmdHandlerFn =
    Arc<dyn for<'a> Fn(BoxAnySend, &'a AppContext) -> CmdHandlerFuture<'a> + Send + Sync>;

/// 基于内存的 CommandBus 实现
/// - 通过 TypeId 注册不同 Command 对应的 Handler（每种命令至多一个）
/// - 运行时以类型擦除（Any）方式进行调度，并在调用端还原 `C::Output`
pub struct InMemoryCommandBus {
    handlers: DashMap<TypeId, (&'static str, CmdHandlerFn)>,
}

impl Default for InMemoryCommandBus {
    fn default() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }
}

impl InMemoryCommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册命令处理器
    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), AppError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let key = TypeId::of::<C>();

        if self.handlers.contains_key(&key) {
            return Err(AppError::AlreadyRegisteredCommand { command: C::NAME });
        }

        let f: CmdHandlerFn = Arc::new(move |boxed_cmd, ctx| {
            let handler = handler.clone();

            Box::pin(async move {
                // 键与闭包同一泛型 C，downcast 不会失败
                match boxed_cmd.downcast::<C>() {
                    Ok(cmd) => {
                        let output = handler.handle(ctx, *cmd).await?;
                        Ok(Box::new(output) as BoxAnySend)
                    }
                    Err(_) => Err(AppError::TypeMismatch {
                        expected: C::NAME,
                        found: "unknown",
                    }),
                }
            })
        });

        self.handlers.insert(key, (C::NAME, f));

        Ok(())
    }

    /// 已注册的命令名列表（只读视图）
    pub fn registered_commands(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|e| e.value().0).collect()
    }
}

#[async_trait]
impl CommandBus for InMemoryCommandBus {
    async fn dispatch<C>(&self, ctx: &AppContext, cmd: C) -> Result<C::Output, AppError>
    where
        C: Command,
    {
        let Some(f) = self
            .handlers
            .get(&TypeId::of::<C>())
            .map(|h| h.value().1.clone())
        else {
            return Err(AppError::HandlerNotFound(C::NAME));
        };

        let out = (f)(Box::new(cmd), ctx).await?;

        match out.downcast::<C::Output>() {
            Ok(output) => Ok(*output),
            Err(_) => Err(AppError::TypeMismatch {
                expected: type_name::<C::Output>(),
                found: "unknown",
            }),
        }
    }
}
